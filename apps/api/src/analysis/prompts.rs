// Prompt skeletons for resume analysis.
// Placeholders: {resume_text}, {job_description}. Filled once by prompt_builder.

/// Long ATS-style rubric. Default template.
pub const COMPREHENSIVE_TEMPLATE: &str = r#"You are an expert ATS (Applicant Tracking System) consultant and career coach. Provide a comprehensive, professional resume analysis.

**IMPORTANT**: Your analysis should be detailed, actionable, and extensive.

# COMPREHENSIVE RESUME ANALYSIS

## 1. EXECUTIVE SUMMARY
Provide an overall assessment of the resume's strengths and alignment with the job description.

## 2. ATS COMPATIBILITY ANALYSIS
### Overall ATS Score: X/100
- **Keyword Match Score**: X/100 - Analysis of keyword density and relevance
- **Format Compatibility**: Assessment of ATS-friendly formatting
- **Critical Issues**: List any formatting problems that will cause ATS rejection
- **Immediate Fixes**: Top 3 urgent changes needed

## 3. DETAILED SKILLS ANALYSIS

### Required Skills Checklist
For each skill in the job description:
- Skill Name - (Present/Missing)
- Evidence in resume (if present)
- Recommendation for improvement

### Missing Critical Skills (HIGH PRIORITY)
List skills from the job description not found in the resume and explain their importance

### Transferable Skills to Highlight
Identify skills from the resume that apply to this role

## 4. EXPERIENCE ALIGNMENT

### Relevant Experience Breakdown
- Match percentage: X%
- Strongest alignments
- Experience gaps
- Suggestions to reframe existing experience

### Achievement Quantification
- Current quantified achievements found
- Recommendations for adding metrics
- Example bullet point improvements

## 5. KEYWORD OPTIMIZATION STRATEGY

### Current Keywords Present (Matching the job description)
List all matching keywords

### CRITICAL Missing Keywords
- Keyword | Importance | Where to Add | How to Incorporate Naturally

### Keyword Density Recommendations
- Optimal placement strategy
- Sections needing keyword enrichment

## 6. ATS-FRIENDLY FORMATTING CHECKLIST
- Standard section headers
- Simple, clean font
- No tables, text boxes or graphics
- Consistent formatting
- Proper file format (PDF/Word)
- Appropriate length (1-2 pages)

### Formatting Improvements Needed
List specific changes

## 7. CONTENT ENHANCEMENT RECOMMENDATIONS

### Professional Summary Rewrite
Provide an improved summary tailored to the job (3-4 sentences with keywords)

### Work Experience Optimization
For the top 2-3 positions:
- Current bullet analysis
- Improved version with action verbs and metrics
- Missing impact statements

### Skills Section Enhancement
- Technical skills to add
- Soft skills to emphasize
- Certifications needed

## 8. IMMEDIATE ACTION PLAN

### This Week (CRITICAL):
1. [Specific actionable task]
2. [Specific actionable task]
3. [Specific actionable task]

### Next Week (IMPORTANT):
1. [Specific actionable task]
2. [Specific actionable task]

### Month 1 (ENHANCEMENT):
1. [Specific actionable task]
2. [Specific actionable task]

## 9. COMPETITIVE POSITIONING
- Unique value proposition for this role
- How to differentiate from other candidates
- Key talking points for interviews

## 10. POTENTIAL RED FLAGS & SOLUTIONS
- Employment gaps (if any) and how to address them
- Career transition challenges and how to frame them
- Overqualification or underqualification concerns
- Recommended explanations

## 11. INTERVIEW PREPARATION INSIGHTS
Based on the resume:
- Expected interview questions (5-7)
- Key achievements to emphasize
- Stories to prepare (STAR method)

## 12. MATCH ASSESSMENT
- Overall Match Score: X/100
- Match Breakdown:
  * Skills Match: X%
  * Experience Match: X%
  * Education Match: X%
  * Cultural Fit Indicators: X%

## 13. FINAL RECOMMENDATIONS
- Top 3 strengths to emphasize
- Top 3 areas needing immediate improvement
- Timeline to optimize the resume (realistic)
- Success probability if applied today: X%

Resume Content:
{resume_text}

Job Description:
{job_description}

Provide detailed, specific, actionable analysis following this framework."#;

/// Short structured-markdown variant.
pub const CONCISE_TEMPLATE: &str = r#"Compare the resume below against the job description and answer in markdown with exactly these sections:

## Match Score
A single score out of 100 and one sentence explaining it.

## Strengths
3-5 bullets, each tied to a requirement in the job description.

## Gaps
3-5 bullets naming missing skills or experience.

## Recommendations
3 concrete edits to the resume, most important first.

Resume:
{resume_text}

Job Description:
{job_description}"#;
